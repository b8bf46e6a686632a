pub type ChannelIndex = usize;
pub type ExchangeSeqNo = u64;

/// Which session credential a channel carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionScope {
    /// Follows the logged-in account session
    Main,
    /// Follows the session of an opened folder link
    FolderLink,
    /// Never carries a session
    Anonymous,
}

impl SessionScope {
    pub fn follows_main_session(self) -> bool {
        matches!(self, SessionScope::Main)
    }

    pub fn follows_folder_session(self) -> bool {
        matches!(self, SessionScope::FolderLink)
    }
}
