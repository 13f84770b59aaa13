pub mod manager;
pub mod naming;
pub mod receiver;
pub mod reconciler;
pub mod request;

#[cfg(test)]
pub(crate) mod test_support;

pub use manager::{
    DownloadEvent, DownloadManager, DownloadOutcome, DownloadStatus, DownloadSubsystem,
    FailureReason,
};
pub use naming::Extension;
pub use receiver::DownloadReceiver;
pub use reconciler::{reconcile, PrivateStorage, Reconciliation};
pub use request::{parse_playlist_id, playlist_description, DownloadRequest};
