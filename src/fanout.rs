use futures::future::{self, BoxFuture};

use crate::error::{AttemptError, CallError};
use crate::retry::RetryPolicy;

type CallFn<'a, T> = Box<dyn FnMut() -> BoxFuture<'a, Result<T, AttemptError>> + Send + 'a>;

/// One independent branch of a fan-out.
pub struct Branch<'a, T> {
    label: String,
    call: CallFn<'a, T>,
}

impl<'a, T> Branch<'a, T> {
    pub fn new<F>(label: impl Into<String>, call: F) -> Self
    where
        F: FnMut() -> BoxFuture<'a, Result<T, AttemptError>> + Send + 'a,
    {
        Self {
            label: label.into(),
            call: Box::new(call),
        }
    }
}

/// Run every branch concurrently, each under `policy`, and wait for all of them.
///
/// A branch failing does not cancel its siblings. The output has one entry
/// per branch, in input order.
pub async fn join_all<'a, T>(
    policy: &RetryPolicy,
    branches: Vec<Branch<'a, T>>,
) -> Vec<Result<T, CallError>> {
    let calls = branches
        .into_iter()
        .map(|branch| async move { policy.invoke(&branch.label, branch.call).await });
    future::join_all(calls).await
}
