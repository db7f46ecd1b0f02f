pub mod implementations;
