pub mod devbox;
