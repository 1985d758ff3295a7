//! Node metadata, create modes and access control lists.

/// Node metadata as reported by the coordination service.
///
/// `version` is the optimistic-concurrency token checked by `set` and
/// `delete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    /// Transaction id that created the node.
    pub czxid: i64,
    /// Transaction id that last modified the node's data.
    pub mzxid: i64,
    /// Creation time in milliseconds since the epoch.
    pub ctime: i64,
    /// Last modification time in milliseconds since the epoch.
    pub mtime: i64,
    /// Number of changes to the node's data.
    pub version: i32,
    /// Number of changes to the node's children.
    pub cversion: i32,
    /// Number of changes to the node's ACL.
    pub aversion: i32,
    /// Owning session id for ephemeral nodes, zero otherwise.
    pub ephemeral_owner: i64,
    pub data_length: i32,
    pub num_children: i32,
    /// Transaction id that last modified the node's children.
    pub pzxid: i64,
}

impl Stat {
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral_owner != 0
    }
}

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    Persistent,
    Ephemeral,
    PersistentSequential,
    EphemeralSequential,
}

impl CreateMode {
    /// Wire flags understood by the service.
    pub fn flags(&self) -> i32 {
        match self {
            CreateMode::Persistent => 0,
            CreateMode::Ephemeral => 1,
            CreateMode::PersistentSequential => 2,
            CreateMode::EphemeralSequential => 3,
        }
    }

    pub fn from_flags(flags: i32) -> Option<Self> {
        match flags {
            0 => Some(CreateMode::Persistent),
            1 => Some(CreateMode::Ephemeral),
            2 => Some(CreateMode::PersistentSequential),
            3 => Some(CreateMode::EphemeralSequential),
            _ => None,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Permission bits of an [`Acl`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Perms(pub u32);

impl Perms {
    pub const READ: Perms = Perms(1);
    pub const WRITE: Perms = Perms(1 << 1);
    pub const CREATE: Perms = Perms(1 << 2);
    pub const DELETE: Perms = Perms(1 << 3);
    pub const ADMIN: Perms = Perms(1 << 4);
    pub const ALL: Perms = Perms(0x1f);

    pub fn contains(&self, other: Perms) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Perms {
    type Output = Perms;

    fn bitor(self, rhs: Perms) -> Perms {
        Perms(self.0 | rhs.0)
    }
}

/// One access control entry: `scheme:id` is granted `perms`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acl {
    pub perms: Perms,
    pub scheme: String,
    pub id: String,
}

impl Acl {
    /// Entry for `world:anyone`.
    pub fn world(perms: Perms) -> Self {
        Self {
            perms,
            scheme: "world".to_string(),
            id: "anyone".to_string(),
        }
    }

    /// Entry granting everything to the authenticated creator.
    pub fn creator_all() -> Self {
        Self {
            perms: Perms::ALL,
            scheme: "auth".to_string(),
            id: String::new(),
        }
    }

    /// Fully open ACL: all permissions for everyone.
    pub fn open_unsafe() -> Vec<Acl> {
        vec![Acl::world(Perms::ALL)]
    }

    /// Read-only for everyone.
    pub fn read_unsafe() -> Vec<Acl> {
        vec![Acl::world(Perms::READ)]
    }

    pub fn is_world(&self) -> bool {
        self.scheme == "world" && self.id == "anyone"
    }
}
