//Helpers for building small encoded images in tests
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage, Rgba, RgbaImage};

pub const RED: [u8;3] = [255, 0, 0];
pub const BLUE: [u8;3] = [0, 0, 255];
pub const WHITE: [u8;3] = [255, 255, 255];

fn encode( img: &DynamicImage, format: ImageOutputFormat ) -> Vec<u8> {
	let mut bytes = Cursor::new( Vec::new() );
	img.write_to( &mut bytes, format ).unwrap();
	bytes.into_inner()
}

pub fn solid_png( width: u32, height: u32, colour: [u8;3] ) -> Vec<u8> {
	let [r, g, b] = colour;
	let img = RgbaImage::from_pixel( width, height, Rgba([r, g, b, 255]) );
	encode( &DynamicImage::ImageRgba8( img ), ImageOutputFormat::Png )
}

pub fn solid_jpeg( width: u32, height: u32, colour: [u8;3], quality: u8 ) -> Vec<u8> {
	let img = RgbImage::from_pixel( width, height, Rgb(colour) );
	encode( &DynamicImage::ImageRgb8( img ), ImageOutputFormat::Jpeg( quality ) )
}

//Greyscale ramp running from black on the left to white on the right
pub fn gradient_png( width: u32, height: u32 ) -> Vec<u8> {
	let img = RgbImage::from_fn( width, height, |x, _| {
		let v = ( x * 255 / (width - 1) ) as u8;
		Rgb([v, v, v])
	});
	encode( &DynamicImage::ImageRgb8( img ), ImageOutputFormat::Png )
}

pub fn write_file( dir: &Path, name: &str, bytes: &[u8] ) -> PathBuf {
	let path = dir.join( name );
	std::fs::write( &path, bytes ).unwrap();
	path
}
