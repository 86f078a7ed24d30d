use std::process::ExitCode;

use colored::Colorize;
use serde::Serialize;
use session_auth::SessionError;
use session_http::HttpResponse;

/// How one request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// 2xx answer
    Success,
    /// Any other status the backend answered with
    Status,
    /// Still unauthorized after a refresh
    Unauthorized,
    SessionExpired,
    /// Transport, config or client failure
    Failed,
    /// Not sent because the session had already ended
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub path: String,
    pub kind: OutcomeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Outcome {
    pub async fn from_result(path: String, result: Result<HttpResponse, SessionError>) -> Self {
        match result {
            Ok(response) => {
                let status = response.status();
                let kind = if status.is_success() {
                    OutcomeKind::Success
                } else {
                    OutcomeKind::Status
                };
                let (body_bytes, detail) = match response.bytes().await {
                    Ok(body) => (Some(body.len()), None),
                    Err(err) => (None, Some(err.to_string())),
                };
                Self {
                    path,
                    kind,
                    status: Some(status.as_u16()),
                    body_bytes,
                    detail,
                }
            }
            Err(err) => Self::from_error(path, &err),
        }
    }

    fn from_error(path: String, err: &SessionError) -> Self {
        let (kind, status) = match err {
            SessionError::Authorization { status } => {
                (OutcomeKind::Unauthorized, Some(status.as_u16()))
            }
            SessionError::SessionExpired(_) => (OutcomeKind::SessionExpired, None),
            _ => (OutcomeKind::Failed, None),
        };
        Self {
            path,
            kind,
            status,
            body_bytes: None,
            detail: Some(err.to_string()),
        }
    }

    #[must_use]
    pub fn cancelled(path: String) -> Self {
        Self {
            path,
            kind: OutcomeKind::Cancelled,
            status: None,
            body_bytes: None,
            detail: Some("session ended before the request was sent".to_owned()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Summary {
    pub outcomes: Vec<Outcome>,
    pub session_terminated: bool,
}

impl Summary {
    #[must_use]
    pub fn new(outcomes: Vec<Outcome>, session_terminated: bool) -> Self {
        Self {
            outcomes,
            session_terminated,
        }
    }

    fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    /// 2 if the session ended, 0 if every request succeeded, 1 otherwise.
    #[must_use]
    pub fn exit_code(&self) -> ExitCode {
        if self.session_terminated || self.count(OutcomeKind::SessionExpired) > 0 {
            ExitCode::from(2)
        } else if self.outcomes.iter().all(|o| o.kind == OutcomeKind::Success) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn print(&self) {
        for outcome in &self.outcomes {
            let status = outcome
                .status
                .map_or_else(|| "---".to_owned(), |s| s.to_string());
            let label = match outcome.kind {
                OutcomeKind::Success => "ok".green(),
                OutcomeKind::Status => "status".yellow(),
                OutcomeKind::Unauthorized => "unauthorized".red(),
                OutcomeKind::SessionExpired => "expired".red().bold(),
                OutcomeKind::Failed => "failed".red(),
                OutcomeKind::Cancelled => "cancelled".dimmed(),
            };
            match &outcome.detail {
                Some(detail) => println!("{status} {label:<12} {}  ({detail})", outcome.path),
                None => println!("{status} {label:<12} {}", outcome.path),
            }
        }

        println!();
        println!(
            "  {} ok, {} other status, {} failed",
            self.count(OutcomeKind::Success),
            self.count(OutcomeKind::Status),
            self.outcomes.len()
                - self.count(OutcomeKind::Success)
                - self.count(OutcomeKind::Status),
        );
        if self.session_terminated {
            println!("  {}", "session terminated".red().bold());
        }
    }
}
