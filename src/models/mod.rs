pub mod batch;
pub mod label;
pub mod record;
pub mod row;

pub use batch::{Batch, BatchStatus};
pub use label::{InputItem, LabelItem, LabelRequest};
pub use record::{CredentialId, Outcome, RequestRecord, Route};
pub use row::{Progress, Row, RowId, Table};
