pub mod rules;
pub mod validator;

pub use rules::{is_module_path, ValidationRule};
pub use validator::{RuleFailure, Validator};
