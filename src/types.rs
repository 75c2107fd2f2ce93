use serde::Deserialize;

// =========================================================================
// Identity settings (User/Group)
// =========================================================================

/// A configured user: a numeric uid, a name from the password database, or
/// empty for "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawId")]
pub struct User(pub String);

/// A configured group: a numeric gid, a name from the group database, or
/// empty for "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "RawId")]
pub struct Group(pub String);

impl From<&str> for User {
    fn from(s: &str) -> Self {
        User(s.trim().to_owned())
    }
}
impl From<&str> for Group {
    fn from(s: &str) -> Self {
        Group(s.trim().to_owned())
    }
}
impl From<u32> for User {
    fn from(id: u32) -> Self {
        User(id.to_string())
    }
}
impl From<u32> for Group {
    fn from(id: u32) -> Self {
        Group(id.to_string())
    }
}

// Config files may write `uid = 1000` or `uid = "daemon"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Numeric(u32),
    Name(String),
}

impl From<RawId> for User {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Numeric(id) => id.into(),
            RawId::Name(name) => name.as_str().into(),
        }
    }
}
impl From<RawId> for Group {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Numeric(id) => id.into(),
            RawId::Name(name) => name.as_str().into(),
        }
    }
}

/// How a [`User`] or [`Group`] setting should be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IdSpec<'a> {
    Unchanged,
    Numeric(u32),
    Name(&'a str),
}

pub(crate) fn classify(setting: &str) -> IdSpec<'_> {
    if setting.is_empty() {
        IdSpec::Unchanged
    } else if let Ok(id) = setting.parse::<u32>() {
        IdSpec::Numeric(id)
    } else {
        IdSpec::Name(setting)
    }
}

impl User {
    pub(crate) fn spec(&self) -> IdSpec<'_> {
        classify(&self.0)
    }
}

impl Group {
    pub(crate) fn spec(&self) -> IdSpec<'_> {
        classify(&self.0)
    }
}

// =========================================================================
// Resolved identity
// =========================================================================

/// The numeric `(uid, gid)` the daemon runs as once privileges are dropped.
/// `None` on either half means "keep the current id".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl ProcessIdentity {
    pub fn new(uid: Option<u32>, gid: Option<u32>) -> Self {
        ProcessIdentity { uid, gid }
    }

    /// True when neither uid nor gid is configured.
    pub fn is_unchanged(&self) -> bool {
        self.uid.is_none() && self.gid.is_none()
    }
}
