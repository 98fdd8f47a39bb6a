pub mod psarc;
