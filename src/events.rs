use crate::pty::ChildExit;
use crate::relay::RelayEnd;

/// Things that happen to a running session, reported by its worker threads
#[derive(Debug)]
pub enum SessionEvent {
    /// The agent's output stream ended
    OutputClosed(RelayEnd),
    /// The user's terminal input ended
    InputClosed(RelayEnd),
    /// The agent process exited
    ChildExited(ChildExit),
}
