mod service;
mod support;
