pub mod health;
pub use self::health::health;

pub mod sessions;
pub use self::sessions::{
    ballot, create_session, delete_session, get_session, request_otp, reset_session,
    submit_identity, switch_method, verify_mobile,
};
