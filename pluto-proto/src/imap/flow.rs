use std::sync::Arc;

use pluto_mail::user::UserState;

/// Session states. Commands are dispatched along the state, so a command
/// arriving in the wrong state never reaches its handler.
pub enum State {
    NotAuthenticated,
    Authenticated(Arc<UserState>),
    /// A folder is selected (its canonical name).
    Mailbox(Arc<UserState>, String),
    Logout,
}

pub enum Transition {
    None,
    Authenticate(Arc<UserState>),
    Select(String),
    Logout,
}

#[derive(Debug)]
pub struct InvalidTransition;

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid session state transition")
    }
}

impl std::error::Error for InvalidTransition {}

impl State {
    pub fn apply(self, transition: Transition) -> Result<Self, InvalidTransition> {
        match (self, transition) {
            (state, Transition::None) => Ok(state),
            (_, Transition::Logout) => Ok(State::Logout),
            (State::NotAuthenticated, Transition::Authenticate(user)) => {
                Ok(State::Authenticated(user))
            }
            (State::Authenticated(user), Transition::Select(folder))
            | (State::Mailbox(user, _), Transition::Select(folder)) => {
                Ok(State::Mailbox(user, folder))
            }
            _ => Err(InvalidTransition),
        }
    }
}
