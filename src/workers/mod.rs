pub mod confirmation;
pub mod submission;

pub use confirmation::ConfirmationWorker;
pub use submission::SubmissionWorker;
