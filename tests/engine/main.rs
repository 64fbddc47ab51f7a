
mod listener;
mod registry;
mod session;
