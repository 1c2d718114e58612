//! Page state for one analysis session.
//!
//! Lifecycle: `Idle -> Analyzing -> Success | Error`, and from `Success` or
//! `Error` back to `Analyzing` on the next submit. Only one analysis may be in
//! flight at a time.

use tracing::{info, warn};

use crate::gemini::{AnalysisError, Analyzer};
use crate::image::ImagePayload;
use crate::models::{AnalysisResult, LifecycleState, Section};
use crate::notify::{Clipboard, Notification};

pub const GENERIC_ERROR_MESSAGE: &str = "خطایی در برقراری ارتباط با هوش مصنوعی رخ داد.";
pub const COPIED_MESSAGE: &str = "متن کپی شد";
pub const RESPONSE_COPIED_MESSAGE: &str = "متن پاسخ کپی شد";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDraft {
    pub text: String,
    pub image: Option<ImagePayload>,
}

impl InputDraft {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }
}

/// Snapshot of the draft taken when a submit is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub text: String,
    pub image: Option<ImagePayload>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CopyError {
    #[error("no analysis result to copy from")]
    NoResult,
    #[error("section `{}` has no copy action", .0.key())]
    NotCopyable(Section),
}

#[derive(Debug, Default)]
pub struct ViewController {
    draft: InputDraft,
    state: LifecycleState,
    result: Option<AnalysisResult>,
    error_message: Option<String>,
    notification: Option<Notification>,
}

impl ViewController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn draft(&self) -> &InputDraft {
        &self.draft
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.draft.text = text.into();
    }

    /// Replaces any previously selected image.
    pub fn select_image(&mut self, image: ImagePayload) {
        self.draft.image = Some(image);
    }

    pub fn clear_image(&mut self) {
        self.draft.image = None;
    }

    pub fn notify(&mut self, notification: Notification) {
        self.notification = Some(notification);
    }

    pub fn take_notification(&mut self) -> Option<Notification> {
        self.notification.take()
    }

    /// Returns `None` (and changes nothing) when the draft is empty or an
    /// analysis is already running. The draft itself is kept.
    pub fn begin_submit(&mut self) -> Option<Submission> {
        if self.state == LifecycleState::Analyzing {
            warn!("submit ignored: analysis already in flight");
            return None;
        }
        if self.draft.is_empty() {
            return None;
        }

        self.state = LifecycleState::Analyzing;
        self.result = None;
        self.error_message = None;

        Some(Submission {
            text: self.draft.text.clone(),
            image: self.draft.image.clone(),
        })
    }

    /// Submit from a form post that carries the current text. While an
    /// analysis is running the post is refused and the draft stays as it was.
    pub fn submit_text(&mut self, text: impl Into<String>) -> Option<Submission> {
        if self.state == LifecycleState::Analyzing {
            warn!("submit ignored: analysis already in flight");
            return None;
        }
        self.set_text(text);
        self.begin_submit()
    }

    /// Applies the outcome of the analysis started by `begin_submit`.
    /// Ignored unless an analysis is in flight.
    pub fn finish(&mut self, outcome: Result<AnalysisResult, AnalysisError>) {
        if self.state != LifecycleState::Analyzing {
            warn!("dropping analysis outcome: no analysis in flight");
            return;
        }

        match outcome {
            Ok(result) => {
                self.result = Some(result);
                self.state = LifecycleState::Success;
                info!("analysis succeeded");
            }
            Err(e) => {
                self.result = None;
                self.error_message = Some(user_message(&e));
                self.state = LifecycleState::Error;
                info!("analysis failed: {}", e);
            }
        }
    }

    /// Runs a whole submit in place. Returns `false` if the submit was a no-op.
    pub async fn submit(&mut self, analyzer: &dyn Analyzer) -> bool {
        let Some(submission) = self.begin_submit() else {
            return false;
        };
        let outcome = analyzer
            .analyze(&submission.text, submission.image.as_ref())
            .await;
        self.finish(outcome);
        true
    }

    pub fn copy_section(
        &mut self,
        section: Section,
        clipboard: &mut dyn Clipboard,
    ) -> Result<(), CopyError> {
        if !section.copyable() {
            return Err(CopyError::NotCopyable(section));
        }
        let result = match (&self.state, &self.result) {
            (LifecycleState::Success, Some(result)) => result,
            _ => return Err(CopyError::NoResult),
        };

        clipboard.write_text(result.get(section));
        let message = if section == Section::SuggestedResponse {
            RESPONSE_COPIED_MESSAGE
        } else {
            COPIED_MESSAGE
        };
        self.notification = Some(Notification::success(message));
        Ok(())
    }
}

/// The error's own text, or the generic message when it has none.
pub fn user_message(error: &AnalysisError) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        GENERIC_ERROR_MESSAGE.to_string()
    } else {
        message
    }
}
