// Staff-creation flow - the finite state machine a UI driver walks

//! # Staff-Creation Flow FSM
//!
//! Staff members create applications on behalf of clients through a
//! multi-step flow: pick the application type, find (or register) the
//! client, fill the form, review, confirm and submit. This module models
//! that flow as a pure state machine so any driver - a chat bot, a web
//! form, a test harness - can walk it and call the staff creation handler
//! at the mapped points. The engine itself never depends on the FSM; it is
//! the reference contract for drivers.

use serde::{Deserialize, Serialize};

/// How the driver looks up the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientSearchMethod {
    Phone,
    Name,
    ClientId,
}

/// States of the staff-creation flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationFlowState {
    SelectingApplicationType,
    SelectingSearchMethod,
    EnteringSearchQuery,
    Searching,
    SelectingFromResults,
    ConfirmingClient,
    // New-client sub-flow
    EnteringNewClientName,
    EnteringNewClientPhone,
    EnteringNewClientAddress,
    ConfirmingNewClient,
    // Application form
    FillingApplicationForm,
    Reviewing,
    ConfirmingSubmission,
    Processing,
    Submitted,
    Error,
}

/// Driver events that move the flow forward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CreationFlowEvent {
    TypeSelected,
    SearchMethodSelected { method: ClientSearchMethod },
    QueryEntered,
    /// Search finished with the given number of matches.
    SearchCompleted { matches: usize },
    ResultPicked,
    ClientConfirmed,
    ClientRejected,
    CreateNewClient,
    NameEntered,
    PhoneEntered,
    AddressEntered,
    AddressSkipped,
    NewClientConfirmed,
    FormCompleted,
    ReviewAccepted,
    ReviewEdited,
    SubmissionConfirmed,
    SubmissionSucceeded,
    SubmissionFailed,
    Retry,
}

impl CreationFlowState {
    /// Apply a driver event. Returns the next state, or `None` when the
    /// event is not meaningful in the current state (drivers treat that as
    /// user error and stay put).
    pub fn advance(self, event: &CreationFlowEvent) -> Option<CreationFlowState> {
        use CreationFlowEvent as E;
        use CreationFlowState as S;

        let next = match (self, event) {
            (S::SelectingApplicationType, E::TypeSelected) => S::SelectingSearchMethod,
            (S::SelectingSearchMethod, E::SearchMethodSelected { .. }) => S::EnteringSearchQuery,
            (S::SelectingSearchMethod, E::CreateNewClient) => S::EnteringNewClientName,
            (S::EnteringSearchQuery, E::QueryEntered) => S::Searching,
            (S::Searching, E::SearchCompleted { matches: 0 }) => S::EnteringNewClientName,
            (S::Searching, E::SearchCompleted { matches: 1 }) => S::ConfirmingClient,
            (S::Searching, E::SearchCompleted { .. }) => S::SelectingFromResults,
            (S::SelectingFromResults, E::ResultPicked) => S::ConfirmingClient,
            (S::ConfirmingClient, E::ClientConfirmed) => S::FillingApplicationForm,
            (S::ConfirmingClient, E::ClientRejected) => S::SelectingSearchMethod,
            (S::EnteringNewClientName, E::NameEntered) => S::EnteringNewClientPhone,
            (S::EnteringNewClientPhone, E::PhoneEntered) => S::EnteringNewClientAddress,
            (S::EnteringNewClientAddress, E::AddressEntered)
            | (S::EnteringNewClientAddress, E::AddressSkipped) => S::ConfirmingNewClient,
            (S::ConfirmingNewClient, E::NewClientConfirmed) => S::FillingApplicationForm,
            (S::ConfirmingNewClient, E::ClientRejected) => S::SelectingSearchMethod,
            (S::FillingApplicationForm, E::FormCompleted) => S::Reviewing,
            (S::Reviewing, E::ReviewAccepted) => S::ConfirmingSubmission,
            (S::Reviewing, E::ReviewEdited) => S::FillingApplicationForm,
            (S::ConfirmingSubmission, E::SubmissionConfirmed) => S::Processing,
            (S::Processing, E::SubmissionSucceeded) => S::Submitted,
            (S::Processing, E::SubmissionFailed) => S::Error,
            (S::Error, E::Retry) => S::Reviewing,
            _ => return None,
        };
        Some(next)
    }

    /// Terminal states end the flow session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CreationFlowState::Submitted)
    }
}
