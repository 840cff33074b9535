//! Execute one test and classify the result.
//!
//! `Ok(outcome)` from the payload is a per-test result. An `Err` or a
//! panic is not: it becomes a [`SchedulerError`] and stops the loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use super::{ScheduledTest, SchedulerError};
use crate::checks::Outcome;

pub(crate) async fn execute(item: &mut ScheduledTest) -> Result<Outcome, SchedulerError> {
    let test = item.name().to_string();

    match AssertUnwindSafe(item.test_mut().run()).catch_unwind().await {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(error)) => Err(SchedulerError::Unclassified { test, error }),
        Err(payload) => Err(SchedulerError::Panicked {
            test,
            message: panic_message(payload.as_ref()),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::Test;
    use anyhow::Result;

    #[derive(Debug)]
    enum Behaviour {
        Pass,
        Warn,
        Error,
        Panic,
    }

    #[derive(Debug)]
    struct Scripted(Behaviour);

    #[async_trait::async_trait]
    impl Test for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn run(&mut self) -> Result<Outcome> {
            match self.0 {
                Behaviour::Pass => Ok(Outcome::Success),
                Behaviour::Warn => Ok(Outcome::warning("disk low")),
                Behaviour::Error => Err(anyhow::anyhow!("index out of range")),
                Behaviour::Panic => panic!("payload bug"),
            }
        }
    }

    fn item(b: Behaviour) -> ScheduledTest {
        ScheduledTest::new(0, 0, Box::new(Scripted(b)))
    }

    #[tokio::test]
    async fn test_outcomes_pass_through() {
        assert_eq!(execute(&mut item(Behaviour::Pass)).await.unwrap(), Outcome::Success);
        assert_eq!(
            execute(&mut item(Behaviour::Warn)).await.unwrap(),
            Outcome::warning("disk low")
        );
    }

    #[tokio::test]
    async fn test_error_is_unclassified() {
        let err = execute(&mut item(Behaviour::Error)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Unclassified { ref test, .. } if test == "scripted"));
        assert!(err.to_string().contains("index out of range"));
    }

    #[tokio::test]
    async fn test_panic_is_caught() {
        let err = execute(&mut item(Behaviour::Panic)).await.unwrap_err();
        match err {
            SchedulerError::Panicked { message, .. } => assert_eq!(message, "payload bug"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
