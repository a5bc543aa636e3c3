// src/drivers/mod.rs
// 仪器驱动、扫频控制与结果处理
pub mod analyzer;
pub mod controller;
pub mod error;
pub mod executor;
pub mod plot;
pub mod port;
pub mod report;
pub mod serial;
pub mod simulated;
pub mod store;
// 公开导出常用类型，方便外部调用
pub use analyzer::BodeAnalyzer;
pub use controller::{classify, CancelToken, SweepController};
pub use error::{AnalysisError, MeasurementQualityError, PlotError, SweepError, TransportError};
pub use executor::SweepStepExecutor;
pub use plot::{render_bode_png, save_bode_png, PlotStyle};
pub use port::{ManualPort, MeasurementPort, ScpiLink, ScpiPort};
pub use report::{persist_sweep, replot, write_report, ReportFiles};
pub use serial::SerialLink;
pub use simulated::{LowPassCircuit, SimulatedScope};
pub use store::DatasetStore;
