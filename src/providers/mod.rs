pub mod abstract_api;
