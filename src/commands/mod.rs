// Deployment commands: apply, plan, status, validate
pub mod deploy;
