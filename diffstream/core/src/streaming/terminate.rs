//! Stop requests

use crate::cancel::StopRegistry;
use crate::error::StreamResult;
use crate::session::ConversationId;

/// Close the stop token of a conversation
///
/// Succeeds exactly once per producer; the running [`ChatOrchestrator`]
/// observes the close, persists the cancelled state and ends its stream.
///
/// # Errors
///
/// Returns [`StreamError::SessionNotFound`] if the conversation never
/// started, already ended, or was already terminated.
///
/// [`ChatOrchestrator`]: super::ChatOrchestrator
/// [`StreamError::SessionNotFound`]: crate::error::StreamError::SessionNotFound
pub fn terminate(stops: &StopRegistry, id: &ConversationId) -> StreamResult<()> {
    match stops.terminate(id) {
        Ok(()) => {
            tracing::info!(conversation_id = %id, "Stop token closed");
            Ok(())
        }
        Err(err) => {
            tracing::debug!(conversation_id = %id, error = %err, "Terminate found no live stream");
            Err(err)
        }
    }
}
