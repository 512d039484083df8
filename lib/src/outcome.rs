use std::fmt;

/// Job numbers are handed out by the job source in increasing order, possibly with gaps.
pub type JobNumber = u64;

/// The closed set of categories a failed job can be counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    SchedulingFailure,
    RecoverableStartupFailure,
    ConnectionFailure,
    QuotaExceeded,
    /// A free-text failure reported to an aggregator running in categorized mode.
    Unclassified,
}

impl ErrorCategory {
    pub const COUNT: usize = 5;

    pub const ALL: [ErrorCategory; ErrorCategory::COUNT] = [
        ErrorCategory::SchedulingFailure,
        ErrorCategory::RecoverableStartupFailure,
        ErrorCategory::ConnectionFailure,
        ErrorCategory::QuotaExceeded,
        ErrorCategory::Unclassified,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::SchedulingFailure => "SchedulingFailure",
            ErrorCategory::RecoverableStartupFailure => "RecoverableStartupFailure",
            ErrorCategory::ConnectionFailure => "ConnectionFailure",
            ErrorCategory::QuotaExceeded => "QuotaExceeded",
            ErrorCategory::Unclassified => "Unclassified",
        }
    }

    pub(crate) fn window_attribute(self) -> &'static str {
        match self {
            ErrorCategory::SchedulingFailure => "window.error.SchedulingFailure.count",
            ErrorCategory::RecoverableStartupFailure => {
                "window.error.RecoverableStartupFailure.count"
            }
            ErrorCategory::ConnectionFailure => "window.error.ConnectionFailure.count",
            ErrorCategory::QuotaExceeded => "window.error.QuotaExceeded.count",
            ErrorCategory::Unclassified => "window.error.Unclassified.count",
        }
    }

    pub(crate) fn summary_attribute(self) -> &'static str {
        match self {
            ErrorCategory::SchedulingFailure => "summary.error.SchedulingFailure.count",
            ErrorCategory::RecoverableStartupFailure => {
                "summary.error.RecoverableStartupFailure.count"
            }
            ErrorCategory::ConnectionFailure => "summary.error.ConnectionFailure.count",
            ErrorCategory::QuotaExceeded => "summary.error.QuotaExceeded.count",
            ErrorCategory::Unclassified => "summary.error.Unclassified.count",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Succeeded,
    Failed(ErrorCategory),
    /// Free-text failure. Never empty; see [`JobOutcome::from_messages`].
    Errored(Vec<String>),
}

/// The result of running one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job: JobNumber,
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn succeeded(job: JobNumber) -> Self {
        JobOutcome {
            job,
            status: JobStatus::Succeeded,
        }
    }

    pub fn failed(job: JobNumber, category: ErrorCategory) -> Self {
        JobOutcome {
            job,
            status: JobStatus::Failed(category),
        }
    }

    /// Free-text reporting. A job that reported no messages succeeded.
    pub fn from_messages(job: JobNumber, messages: Vec<String>) -> Self {
        let status = if messages.is_empty() {
            JobStatus::Succeeded
        } else {
            JobStatus::Errored(messages)
        };
        JobOutcome { job, status }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded)
    }

    pub fn messages(&self) -> &[String] {
        match &self.status {
            JobStatus::Errored(messages) => messages,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_match_table_order() {
        for (i, category) in ErrorCategory::ALL.iter().enumerate() {
            assert_eq!(category.index(), i);
            assert!(category.window_attribute().contains(category.as_str()));
            assert!(category.summary_attribute().contains(category.as_str()));
        }
    }

    #[test]
    fn empty_message_list_is_success() {
        assert!(JobOutcome::from_messages(7, vec![]).is_success());

        let outcome = JobOutcome::from_messages(8, vec!["disk full".into()]);
        assert!(!outcome.is_success());
        assert_eq!(outcome.messages(), ["disk full".to_owned()]);
    }
}
