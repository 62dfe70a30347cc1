//! setup -> run_test -> teardown state machine.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, warn};

use super::{TestStatus, TestUnit, UnitContext, UnitError, UnitRecord};

/// How a single phase ended.
enum Phase {
    Ok,
    Assertion(String),
    Error(String),
}

impl Phase {
    fn from_result(result: Result<Result<(), UnitError>, Box<dyn Any + Send>>) -> Self {
        match result {
            Ok(Ok(())) => Phase::Ok,
            Ok(Err(UnitError::Assertion(failure))) => Phase::Assertion(failure.message),
            Ok(Err(UnitError::Other(e))) => Phase::Error(format!("{:#}", e)),
            Err(panic) => Phase::Error(format!("panicked: {}", panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Execute one unit through its full lifecycle and return its record.
///
/// * setup failure -> `error`; body and teardown never run
/// * assertion failure in the body -> `failed`
/// * any other body failure or panic -> `error`
/// * teardown failure escalates `passed` to `error` and is only logged after
///   `failed`/`error`
///
/// Skipping is decided by the caller before this is invoked.
pub async fn execute(
    unit: &mut (dyn TestUnit + '_),
    ctx: &UnitContext,
    timeout: Duration,
) -> UnitRecord {
    let mut record = UnitRecord::pending(unit.name(), timeout);
    record.start(Utc::now());
    debug!(unit = %record.name, "setup");

    let setup = Phase::from_result(AssertUnwindSafe(unit.setup(ctx)).catch_unwind().await);
    match setup {
        Phase::Ok => {}
        Phase::Assertion(msg) | Phase::Error(msg) => {
            warn!(unit = %record.name, error = %msg, "setup failed; skipping body and teardown");
            record.metadata = ctx.snapshot();
            record.finish(
                TestStatus::Error,
                Some(format!("setup failed: {}", msg)),
                Utc::now(),
            );
            return record;
        }
    }

    debug!(unit = %record.name, "run_test");
    let body = Phase::from_result(AssertUnwindSafe(unit.run_test(ctx)).catch_unwind().await);
    let (mut status, mut message) = match body {
        Phase::Ok => (TestStatus::Passed, None),
        Phase::Assertion(msg) => (TestStatus::Failed, Some(msg)),
        Phase::Error(msg) => (TestStatus::Error, Some(msg)),
    };

    debug!(unit = %record.name, "teardown");
    let teardown = Phase::from_result(AssertUnwindSafe(unit.teardown(ctx)).catch_unwind().await);
    match teardown {
        Phase::Ok => {}
        Phase::Assertion(msg) | Phase::Error(msg) => {
            if status == TestStatus::Passed {
                warn!(unit = %record.name, error = %msg, "teardown failed; marking unit as error");
                status = TestStatus::Error;
                message = Some(format!("teardown failed: {}", msg));
            } else {
                warn!(unit = %record.name, error = %msg, %status, "teardown failed after unsuccessful body");
            }
        }
    }

    record.metadata = ctx.snapshot();
    record.finish(status, message, Utc::now());
    record
}
