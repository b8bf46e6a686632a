use apilane_shared::{ApiCode, ApiError};
use serde_json::Value;

use crate::channel::{
    backoff::RetryCause,
    command::{CommandResult, Shape},
};

/// Field of an explicit per-command error object
const ERROR_FIELD: &str = "err";

/// What the channel does with a complete response.
#[derive(Debug, PartialEq)]
pub(crate) enum Verdict {
    /// Sleep for the backoff, then send the same exchange again
    Retry(RetryCause),
    /// One result per in-flight command, in order
    Settle(Vec<CommandResult>),
    /// The body does not fit the exchange; escalate to a reload
    Malformed(String),
}

pub(crate) fn match_response(shape: Shape, response: Value) -> Verdict {
    let command_count = match shape {
        Shape::Array { commands } => commands,
        Shape::Batch { .. } | Shape::Direct => 1,
    };

    // a bare negative number answers for the whole request
    if let Some(code) = negative_code(&response) {
        let code = match ApiCode::try_from_i64(code) {
            Ok(code) => code,
            Err(err) => return Verdict::Malformed(err.to_string()),
        };
        if code.is_rate_limit() {
            return Verdict::Retry(RetryCause::RateLimited);
        }
        if code.is_transient() {
            return Verdict::Retry(RetryCause::Transient);
        }
        return Verdict::Settle(
            (0..command_count)
                .map(|_| Err(ApiError::Application { code }))
                .collect(),
        );
    }

    match shape {
        Shape::Direct => Verdict::Settle(vec![command_result(response)]),
        Shape::Array { commands } => {
            let Value::Array(results) = response else {
                return Verdict::Malformed(format!(
                    "expected an array of {} results",
                    commands
                ));
            };
            if results.len() != commands {
                return Verdict::Malformed(format!(
                    "{} results for {} commands",
                    results.len(),
                    commands
                ));
            }
            Verdict::Settle(results.into_iter().map(command_result).collect())
        }
        Shape::Batch { slots } => {
            let Value::Array(results) = response else {
                return Verdict::Malformed(format!("expected an array of {} results", slots));
            };
            if results.len() > slots {
                return Verdict::Malformed(format!(
                    "{} results for a batch of {}",
                    results.len(),
                    slots
                ));
            }
            let failed_at = results
                .iter()
                .position(|result| negative_code(result).is_some() || error_code(result).is_some());
            if let Some(index) = failed_at.or_else(|| (results.len() < slots).then_some(results.len())) {
                return Verdict::Settle(vec![Err(ApiError::RolledBack { index })]);
            }
            Verdict::Settle(vec![Ok(Value::Array(results))])
        }
    }
}

fn command_result(result: Value) -> CommandResult {
    if let Some(code) = negative_code(&result).or_else(|| error_code(&result)) {
        return Err(ApiError::application(code));
    }
    Ok(result)
}

fn negative_code(value: &Value) -> Option<i64> {
    value.as_i64().filter(|code| *code < 0)
}

fn error_code(value: &Value) -> Option<i64> {
    value
        .as_object()?
        .get(ERROR_FIELD)?
        .as_i64()
        .filter(|code| *code < 0)
}
