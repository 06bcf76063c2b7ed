mod inspect_cmd;
mod lookup_cmd;

pub use inspect_cmd::cmd_inspect;
pub use lookup_cmd::cmd_lookup;
