pub mod run;
pub mod status;
pub mod terminate;
pub mod validate;
