use meshchat_shared::{DescriptionKind, ProtocolError, SessionDescription, SignalRequest};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    New,
    OfferSent,
    OfferReceived,
    Answered,
    Established,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Sends the offer and opens the text channel.
    Initiator,
    /// Answers a received offer.
    Responder,
}

/// Offer/answer state machine for one remote participant.
#[derive(Debug)]
pub struct Negotiator {
    local: String,
    remote: String,
    role: Role,
    state: NegotiationState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
}

#[derive(Debug)]
pub enum NegotiationAction {
    /// Apply the remote offer, then create an answer.
    AcceptOffer(SessionDescription),
    /// Apply the remote answer, then open the text channel.
    ApplyAnswer(SessionDescription),
    /// Send this envelope through the relay.
    Signal(SignalRequest),
    Ignore,
}

impl Negotiator {
    pub fn initiator(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self::new(local.into(), remote.into(), Role::Initiator)
    }

    pub fn responder(local: impl Into<String>, remote: impl Into<String>) -> Self {
        Self::new(local.into(), remote.into(), Role::Responder)
    }

    fn new(local: String, remote: String, role: Role) -> Self {
        Self {
            local,
            remote,
            role,
            state: NegotiationState::New,
            local_description: None,
            remote_description: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn is_established(&self) -> bool {
        self.state == NegotiationState::Established
    }

    /// The transport finished creating the local description.
    pub fn on_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<NegotiationAction, ProtocolError> {
        match (self.role, self.state, description.kind) {
            (Role::Initiator, NegotiationState::New, DescriptionKind::Offer) => {
                let request = SignalRequest::offer(&self.local, &self.remote, &description)?;
                self.local_description = Some(description);
                self.state = NegotiationState::OfferSent;
                debug!(remote = %self.remote, "Sending offer");
                Ok(NegotiationAction::Signal(request))
            }
            (Role::Responder, NegotiationState::OfferReceived, DescriptionKind::Answer) => {
                let request = SignalRequest::answer(&self.local, &self.remote, &description)?;
                self.local_description = Some(description);
                self.state = NegotiationState::Established;
                debug!(remote = %self.remote, "Sending answer");
                Ok(NegotiationAction::Signal(request))
            }
            (role, state, kind) => {
                debug!(
                    remote = %self.remote,
                    ?role,
                    ?state,
                    ?kind,
                    "Ignoring local description"
                );
                Ok(NegotiationAction::Ignore)
            }
        }
    }

    pub fn on_offer(&mut self, description: SessionDescription) -> NegotiationAction {
        if self.role != Role::Responder || self.state != NegotiationState::New {
            debug!(remote = %self.remote, state = ?self.state, "Ignoring offer");
            return NegotiationAction::Ignore;
        }

        self.remote_description = Some(description.clone());
        self.state = NegotiationState::OfferReceived;
        debug!(remote = %self.remote, "Received offer");
        NegotiationAction::AcceptOffer(description)
    }

    pub fn on_answer(&mut self, description: SessionDescription) -> NegotiationAction {
        if self.role != Role::Initiator || self.state != NegotiationState::OfferSent {
            debug!(remote = %self.remote, state = ?self.state, "Ignoring stale answer");
            return NegotiationAction::Ignore;
        }

        self.remote_description = Some(description.clone());
        self.state = NegotiationState::Answered;
        debug!(remote = %self.remote, "Received answer");
        NegotiationAction::ApplyAnswer(description)
    }

    /// The answer was applied and the text channel requested.
    pub fn mark_established(&mut self) {
        if self.state == NegotiationState::Answered {
            self.state = NegotiationState::Established;
        }
    }

    pub fn close(&mut self) {
        self.state = NegotiationState::Closed;
    }
}
