pub(crate) mod answers;
pub(crate) mod exams;
pub(crate) mod invitations;
pub(crate) mod questions;
pub(crate) mod sessions;
pub(crate) mod users;
