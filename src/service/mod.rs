pub mod inbox_service;
