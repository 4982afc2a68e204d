pub mod dashboard;
pub mod fee_form;
pub mod fees;
pub mod form;
