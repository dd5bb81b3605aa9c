mod cluster;
mod registry;
