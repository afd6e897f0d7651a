pub mod db;
pub mod init;
pub mod migrate;
pub mod project;
pub mod submodule;
