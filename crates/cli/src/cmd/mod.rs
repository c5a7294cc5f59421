mod show;
mod status;

pub use show::cmd_show;
pub use status::cmd_status;
