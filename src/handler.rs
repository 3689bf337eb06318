// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Executor and Validator Seams
//!
//! This module defines the two user-supplied seams of the RPC server: the
//! executor that turns a request body into a response body, and the optional
//! content validator that decides whether a body is handed to the executor at
//! all. Both contracts are expressed through the type system, so a handler
//! with the wrong shape is a compile error rather than a runtime check.
//!
//! Plain closures implement both traits, so most applications never name
//! these types:
//!
//! ```ignore
//! let server = Server::new(cfg, |body: Vec<u8>| async move { Ok(body) })?;
//! ```

use async_trait::async_trait;
use std::future::Future;
use thiserror::Error;

/// A failure raised by an executor while handling a request.
///
/// The failure message becomes the body of the error reply sent to the RPC
/// caller, so it should be meaningful to the calling side.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ExecutionError(pub String);

impl From<&str> for ExecutionError {
    fn from(message: &str) -> Self {
        ExecutionError(message.to_owned())
    }
}

impl From<String> for ExecutionError {
    fn from(message: String) -> Self {
        ExecutionError(message)
    }
}

/// Handles one request body and produces the reply body.
///
/// The executor is invoked after the delivery has been acknowledged; a
/// failure is converted into a JSON error reply and never crashes the server.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Executor: Send + Sync {
    async fn exec(&self, body: Vec<u8>) -> Result<Vec<u8>, ExecutionError>;
}

#[async_trait]
impl<F, Fut> Executor for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<u8>, ExecutionError>> + Send,
{
    async fn exec(&self, body: Vec<u8>) -> Result<Vec<u8>, ExecutionError> {
        self(body).await
    }
}

/// Decides whether a request body is acceptable for the executor.
///
/// Returning `false` rejects the delivery and informs the sender with the
/// `invalid_message_content` error reply. When no validator is configured all
/// content is accepted.
pub trait ContentValidator: Send + Sync {
    fn validate(&self, body: &[u8]) -> bool;
}

impl<F> ContentValidator for F
where
    F: Fn(&[u8]) -> bool + Send + Sync,
{
    fn validate(&self, body: &[u8]) -> bool {
        self(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closures_implement_executor() {
        let identity = |body: Vec<u8>| async move { Ok(body) };
        let out = identity.exec(b"ping".to_vec()).await.unwrap();
        assert_eq!(out, b"ping");
    }

    #[tokio::test]
    async fn executor_failures_carry_their_message() {
        let failing = |_body: Vec<u8>| async move {
            Err::<Vec<u8>, ExecutionError>(ExecutionError::from("bad input"))
        };
        let err = failing.exec(b"ping".to_vec()).await.unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn closures_implement_validator() {
        let validator = |body: &[u8]| body.len() > 1;
        assert!(validator.validate(b"ab"));
        assert!(!validator.validate(b"a"));
    }
}
