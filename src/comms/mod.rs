pub mod gateway_api;
