pub mod greendex;
pub mod raster;
pub mod road;
pub mod table;
pub mod vector;
pub mod vegetation;
