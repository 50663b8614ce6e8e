// ============ Object IDs ============
// Every heap object is addressed by a slot index plus the generation the
// slot had when the object was allocated. A freed slot bumps its
// generation, so a stale handle can never alias a newer object.

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
            pub struct $name {
                pub(crate) index: u32,
                pub(crate) generation: u32,
            }

            impl $name {
                #[inline(always)]
                pub(crate) fn new(index: u32, generation: u32) -> Self {
                    Self { index, generation }
                }

                #[inline(always)]
                pub fn index(self) -> u32 {
                    self.index
                }
            }
        )*
    };
}

define_id!(
    /// Interned string
    StringId,
    TableId,
    /// Lua or native closure
    FunctionId,
    UpvalueId,
    UserdataId,
    /// Coroutine (or the main thread)
    ThreadId,
);

/// Object type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcType {
    String = 0,
    Table = 1,
    Function = 2,
    Upvalue = 3,
    Thread = 4,
    Userdata = 5,
}

/// Unified GC object identifier, used by the gray lists
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcId {
    StringId(StringId),
    TableId(TableId),
    FunctionId(FunctionId),
    UpvalueId(UpvalueId),
    ThreadId(ThreadId),
    UserdataId(UserdataId),
}

impl GcId {
    #[inline(always)]
    pub fn gc_type(self) -> GcType {
        match self {
            GcId::StringId(_) => GcType::String,
            GcId::TableId(_) => GcType::Table,
            GcId::FunctionId(_) => GcType::Function,
            GcId::UpvalueId(_) => GcType::Upvalue,
            GcId::ThreadId(_) => GcType::Thread,
            GcId::UserdataId(_) => GcType::Userdata,
        }
    }
}

impl From<StringId> for GcId {
    fn from(id: StringId) -> Self {
        GcId::StringId(id)
    }
}

impl From<TableId> for GcId {
    fn from(id: TableId) -> Self {
        GcId::TableId(id)
    }
}

impl From<FunctionId> for GcId {
    fn from(id: FunctionId) -> Self {
        GcId::FunctionId(id)
    }
}

impl From<UpvalueId> for GcId {
    fn from(id: UpvalueId) -> Self {
        GcId::UpvalueId(id)
    }
}

impl From<ThreadId> for GcId {
    fn from(id: ThreadId) -> Self {
        GcId::ThreadId(id)
    }
}

impl From<UserdataId> for GcId {
    fn from(id: UserdataId) -> Self {
        GcId::UserdataId(id)
    }
}
