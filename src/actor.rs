use futures::FutureExt;
use std::any::Any;
use std::fmt::{self, Debug, Display, Formatter};
use std::panic::AssertUnwindSafe;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ActorError {
    #[error("pre-start initialization failed: {0}")]
    PreStartFailed(String),
    #[error("post-stop cleanup failed: {0}")]
    PostStopFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorStatus {
    PreStartFailed,
    Running,
    ExitedGracefully,
    ExitedWithError,
    Panicked,
    PostStopFailed,
    ShutDown,
}

impl Display for ActorStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ActorStatus::PreStartFailed => "pre_start_failed",
            ActorStatus::Running => "running",
            ActorStatus::ExitedGracefully => "exited_gracefully",
            ActorStatus::ExitedWithError => "exited_with_error",
            ActorStatus::Panicked => "panicked",
            ActorStatus::PostStopFailed => "post_stop_failed",
            ActorStatus::ShutDown => "shut_down",
        })
    }
}

/// A long-lived worker owning its own state and a mailbox.
///
/// Everything outside the actor talks to it through a cloneable handle; the
/// actor is the only writer of its fields.
pub trait Actor: Send + Sized {
    type ID: Display + Debug + Clone + Send + Sync + 'static;

    fn kind(&self) -> &'static str;

    fn id(&self) -> Self::ID;

    fn pre_start(&mut self) -> impl Future<Output = Result<(), ActorError>> + Send {
        async { Ok(()) }
    }

    fn run(&mut self) -> impl Future<Output = Result<(), ActorError>> + Send;

    /// Runs after `run` returns, after `pre_start` fails, and after a panic in
    /// `run`. Must tolerate half-updated state.
    fn post_stop(&mut self) -> impl Future<Output = Result<(), ActorError>> + Send {
        async { Ok(()) }
    }
}

/// Drives an actor through its lifecycle and returns its final status.
pub async fn run<A>(actor: A) -> ActorStatus
where
    A: Actor + 'static,
{
    let kind = actor.kind();
    let id = actor.id();
    run_instrumented(actor, kind, id).await
}

#[tracing::instrument(
    name = "actor_run",
    skip_all,
    fields(
        actor.kind = %kind,
        actor.id = %id,
        status = tracing::field::Empty,
    )
)]
async fn run_instrumented<A>(mut actor: A, kind: &'static str, id: A::ID) -> ActorStatus
where
    A: Actor + 'static,
{
    let span = tracing::Span::current();
    tracing::debug!("starting actor");

    let mut status = match actor.pre_start().await {
        Ok(()) => ActorStatus::Running,
        Err(err) => {
            tracing::error!(error = %err, "pre_start failed");
            ActorStatus::PreStartFailed
        }
    };
    span.record("status", tracing::field::display(status));

    if status == ActorStatus::Running {
        status = match AssertUnwindSafe(actor.run()).catch_unwind().await {
            Ok(Ok(())) => ActorStatus::ExitedGracefully,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "actor exited with an error");
                ActorStatus::ExitedWithError
            }
            Err(payload) => {
                tracing::error!(panic.message = %panic_message(&payload), "actor panicked");
                ActorStatus::Panicked
            }
        };
        span.record("status", tracing::field::display(status));
    }

    match actor.post_stop().await {
        Ok(()) if status == ActorStatus::ExitedGracefully => status = ActorStatus::ShutDown,
        Ok(()) => {}
        Err(err) => {
            tracing::warn!(error = %err, "post_stop failed");
            if status == ActorStatus::ExitedGracefully {
                status = ActorStatus::PostStopFailed;
            }
        }
    }

    span.record("status", tracing::field::display(status));
    tracing::debug!("actor shut down with final status: {status}");
    status
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{:?}", payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Scripted {
        fail_start: bool,
        panic_in_run: bool,
        stopped: bool,
    }

    impl Actor for Scripted {
        type ID = &'static str;

        fn kind(&self) -> &'static str {
            "scripted"
        }

        fn id(&self) -> Self::ID {
            "test"
        }

        async fn pre_start(&mut self) -> Result<(), ActorError> {
            if self.fail_start {
                return Err(ActorError::PreStartFailed("nope".to_string()));
            }
            Ok(())
        }

        async fn run(&mut self) -> Result<(), ActorError> {
            if self.panic_in_run {
                panic!("boom");
            }
            Ok(())
        }

        async fn post_stop(&mut self) -> Result<(), ActorError> {
            self.stopped = true;
            Ok(())
        }
    }

    fn scripted(fail_start: bool, panic_in_run: bool) -> Scripted {
        Scripted {
            fail_start,
            panic_in_run,
            stopped: false,
        }
    }

    #[tokio::test]
    async fn graceful_run_shuts_down() {
        assert_eq!(run(scripted(false, false)).await, ActorStatus::ShutDown);
    }

    #[tokio::test]
    async fn failed_pre_start_skips_run() {
        assert_eq!(run(scripted(true, true)).await, ActorStatus::PreStartFailed);
    }

    #[tokio::test]
    async fn panic_is_captured() {
        assert_eq!(run(scripted(false, true)).await, ActorStatus::Panicked);
    }
}
