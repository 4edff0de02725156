mod db_upgrade;

pub use db_upgrade::*;
