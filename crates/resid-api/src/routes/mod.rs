//! # API Route Modules
//!
//! | Prefix | Module |
//! |--------|--------|
//! | `/v1/credentials/*` | [`credentials`] |
//! | `/v1/subjects/*` | [`subjects`] |

pub mod credentials;
pub mod subjects;
