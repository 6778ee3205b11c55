mod envelope;
mod record;
mod source;

pub use envelope::Envelope;
pub use envelope::EnvelopeKind;
pub use envelope::EnvelopeState;
pub use record::Attachment;
pub use record::CanonicalDoc;
pub use record::CanonicalEmail;
pub use record::CanonicalRecord;
pub use record::CanonicalTask;
pub use source::Source;
