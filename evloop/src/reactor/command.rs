use super::timer::TimerEntry;

/// Requests sent from any thread to the dispatching thread.
///
/// Registration of descriptors does not go through here: the pollers
/// accept it directly from any thread.
pub(crate) enum Command {
    SetTimer(TimerEntry),
    Exit,
}
