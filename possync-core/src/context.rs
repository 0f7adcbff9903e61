/// Who is performing a local mutation and from which device.
///
/// Every version bump records `device_id` in the entity's vector clock, so the
/// context is always passed in explicitly rather than read from process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationContext {
    pub user_id: String,
    pub device_id: String,
}

impl MutationContext {
    pub fn new(user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }
}
