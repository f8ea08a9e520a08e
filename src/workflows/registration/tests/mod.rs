mod common;
mod services;
