pub mod codec;
pub mod gateway;
pub mod issuance;
pub mod progress;
pub mod qr;
pub mod service;
pub mod sheet;
pub mod validation;

pub use codec::{CodecError, QrPayload, ScanCode};
pub use gateway::{
    CreatedRecords, DeleteError, DeletionReport, IncompleteBatch, PersistError, PersistenceGateway,
};
pub use issuance::{IssuanceEngine, IssuanceError, TicketDraft, TierMapping};
pub use progress::{IssuanceStatus, Progress, ProgressError, ProgressTracker};
pub use qr::{QrRenderer, RenderError};
pub use service::{DocumentPipeline, IssuanceReport, IssuanceService, RunError, StageError};
pub use sheet::HtmlSheetRenderer;
pub use validation::{ScanOutcome, ValidationResolver};
