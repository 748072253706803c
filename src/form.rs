//! Record editor state.
//!
//! One value per screen replaces separate modal/edit/draft flags:
//! `Idle -> ModalOpen -> Submitting -> Idle | Error`.

use uuid::Uuid;

use crate::error::{GradebookError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormState<D> {
    Idle,
    ModalOpen { mode: FormMode, draft: D },
    Submitting { mode: FormMode, draft: D },
    Error { mode: FormMode, draft: D, message: String },
}

impl<D> Default for FormState<D> {
    fn default() -> Self {
        FormState::Idle
    }
}

impl<D: Clone> FormState<D> {
    pub fn name(&self) -> &'static str {
        match self {
            FormState::Idle => "Idle",
            FormState::ModalOpen { .. } => "ModalOpen",
            FormState::Submitting { .. } => "Submitting",
            FormState::Error { .. } => "Error",
        }
    }

    fn invalid(&self, event: &'static str) -> GradebookError {
        GradebookError::InvalidTransition {
            from: self.name(),
            event,
        }
    }

    pub fn open_create(&mut self, draft: D) -> Result<()> {
        self.open(FormMode::Create, draft, "open_create")
    }

    pub fn open_edit(&mut self, id: Uuid, draft: D) -> Result<()> {
        self.open(FormMode::Edit(id), draft, "open_edit")
    }

    fn open(&mut self, mode: FormMode, draft: D, event: &'static str) -> Result<()> {
        match self {
            FormState::Idle => {
                *self = FormState::ModalOpen { mode, draft };
                Ok(())
            }
            _ => Err(self.invalid(event)),
        }
    }

    pub fn draft_mut(&mut self) -> Option<&mut D> {
        match self {
            FormState::ModalOpen { draft, .. } => Some(draft),
            _ => None,
        }
    }

    /// Moves to `Submitting` and hands back what should be sent.
    pub fn submit(&mut self) -> Result<(FormMode, D)> {
        match self {
            FormState::ModalOpen { mode, draft } => {
                let (mode, draft) = (*mode, draft.clone());
                *self = FormState::Submitting {
                    mode,
                    draft: draft.clone(),
                };
                Ok((mode, draft))
            }
            _ => Err(self.invalid("submit")),
        }
    }

    /// Closes the form and clears the draft.
    pub fn complete(&mut self) -> Result<()> {
        match self {
            FormState::Submitting { .. } => {
                *self = FormState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("complete")),
        }
    }

    /// Validation or store failure; the draft is kept for another attempt.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        match self {
            FormState::ModalOpen { mode, draft } | FormState::Submitting { mode, draft } => {
                *self = FormState::Error {
                    mode: *mode,
                    draft: draft.clone(),
                    message: message.into(),
                };
                Ok(())
            }
            _ => Err(self.invalid("fail")),
        }
    }

    pub fn retry(&mut self) -> Result<()> {
        match self {
            FormState::Error { mode, draft, .. } => {
                *self = FormState::ModalOpen {
                    mode: *mode,
                    draft: draft.clone(),
                };
                Ok(())
            }
            _ => Err(self.invalid("retry")),
        }
    }

    pub fn cancel(&mut self) -> Result<()> {
        match self {
            FormState::ModalOpen { .. } | FormState::Error { .. } => {
                *self = FormState::Idle;
                Ok(())
            }
            _ => Err(self.invalid("cancel")),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            FormState::Error { message, .. } => Some(message),
            _ => None,
        }
    }
}
