//! 基础设施层（Infrastructure）
//!
//! 持有文件系统与时间这类底层能力，只暴露能力，不含业务判断

pub mod atomic_file;
pub mod codec;
pub mod sleeper;

pub use atomic_file::write_atomic;
pub use codec::{CodecError, CsvCodec, TableCodec};
pub use sleeper::{sleep_or_cancel, RecordingSleeper, Sleeper, TokioSleeper};
