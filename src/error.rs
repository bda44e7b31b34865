use crate::platform::ResourceKind;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to get CR: {0}")]
    CRGetFailed(#[source] kube::Error),
    #[error("MissingObjectKey: {0}")]
    MissingObjectKey(&'static str),

    #[error("Failed to create {0} {1}: {2}")]
    CreateResourceFailed(ResourceKind, String, #[source] kube::Error),
    #[error("Failed to get {0} {1}: {2}")]
    GetResourceFailed(ResourceKind, String, #[source] kube::Error),
    #[error("Failed to update {0} {1}: {2}")]
    ReplaceResourceFailed(ResourceKind, String, #[source] kube::Error),
    #[error("Failed to delete {0} {1}: {2}")]
    DeleteResourceFailed(ResourceKind, String, #[source] kube::Error),
    #[error("{0} {1} not found")]
    ResourceNotFound(ResourceKind, String),
    #[error("Failed to list pods: {0}")]
    ListPodsFailed(#[source] kube::Error),
    #[error("Failed to delete pod {0}: {1}")]
    DeletePodFailed(String, #[source] kube::Error),
    #[error("Failed to get secret {0}: {1}")]
    GetSecretFailed(String, #[source] kube::Error),
    #[error("Failed to watch secrets: {0}")]
    WatchSecretFailed(#[source] kube::Error),

    #[error("can not find {field} for Graylog in the secret {secret} in the namespace {namespace}")]
    MissingGraylogCredential {
        field: &'static str,
        secret: String,
        namespace: String,
    },
    #[error("Failed to resolve credentials: {0}")]
    CredentialResolveFailed(String),
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0} is not started")]
    NotStarted(String),
    #[error("graylog has not scaled down")]
    NotScaledDown,
    #[error("mongo upgrade job {0} failed")]
    MigrationJobFailed(String),
    #[error("Host {0} is unreachable: {1}")]
    HostUnreachable(String, #[source] std::io::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClientBuildFailed(#[source] reqwest::Error),
    #[error("Failed to {0}: {1}")]
    RequestFailed(String, #[source] reqwest::Error),
    #[error("Failed to {operation}: unexpected status code {status}")]
    UnexpectedStatus { operation: String, status: u16 },
    #[error("{0}")]
    Precondition(String),
    #[error("Failed to parse {0}: {1}")]
    ParseFailed(String, #[source] serde_json::Error),
    #[error("Failed to extract archive {0}: {1}")]
    ArchiveFailed(String, #[source] zip::result::ZipError),
    #[error("{0}: illegal file path")]
    IllegalArchivePath(String),
    #[error("{0}: archive entry is larger than {1} bytes")]
    ArchiveEntryTooLarge(String, u64),
    #[error("Failed to {0}: {1}")]
    Io(String, #[source] std::io::Error),
}

impl Error {
    pub fn unexpected_status(operation: impl Into<String>, status: u16) -> Self {
        Error::UnexpectedStatus {
            operation: operation.into(),
            status,
        }
    }

    pub fn io(operation: impl Into<String>, err: std::io::Error) -> Self {
        Error::Io(operation.into(), err)
    }
}
