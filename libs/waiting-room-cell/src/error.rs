use shared_models::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WaitingRoomError {
    #[error("Queue store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Queue store pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Appointment store error: {0}")]
    Directory(String),

    #[error("No patient record resolved for user {0}")]
    PatientResolution(String),
}

impl From<WaitingRoomError> for AppError {
    fn from(err: WaitingRoomError) -> Self {
        match err {
            WaitingRoomError::Store(_) | WaitingRoomError::Pool(_) => {
                AppError::ExternalService("Queue store unavailable".to_string())
            }
            WaitingRoomError::Serialization(e) => AppError::Internal(e.to_string()),
            WaitingRoomError::Directory(e) => AppError::ExternalService(e),
            WaitingRoomError::PatientResolution(user) => {
                AppError::NotFound(format!("No patient record for user {}", user))
            }
        }
    }
}
