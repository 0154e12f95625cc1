//! API request handlers

pub mod ssh;

pub use ssh::{
    sign_ssh, ssh_config, ssh_keys, AppState, SignSshRequest, SignSshResponse, SshAuthority,
    SshConfigRequest, SshConfigResponse, SshKeysResponse,
};
