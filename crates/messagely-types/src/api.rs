use serde::{Deserialize, Serialize};

use crate::models::{MessageDetail, NewMessage, ReadReceipt, ReceivedMessage, SentMessage, User, UserSummary};

// -- JWT Claims --

/// The only claim carried by a session token. No expiry is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
}

// -- Auth --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

// -- Users --

#[derive(Debug, Serialize, Deserialize)]
pub struct UsersResponse {
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SentMessagesResponse {
    pub messages: Vec<SentMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceivedMessagesResponse {
    pub messages: Vec<ReceivedMessage>,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub to_username: String,
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse<T> {
    pub message: T,
}

pub type MessageDetailResponse = MessageResponse<MessageDetail>;
pub type NewMessageResponse = MessageResponse<NewMessage>;
pub type ReadReceiptResponse = MessageResponse<ReadReceipt>;

// -- Errors --

/// Body of every error response: `{"error": {"message": ..., "status": ...}}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub status: u16,
}
