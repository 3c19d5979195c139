use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba([12, 200, 90, 255]));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .expect("encode png");
    buffer
}

/// PNG with a zip archive and a script appended after the image data.
pub fn png_polyglot() -> Vec<u8> {
    let mut bytes = png(8, 8);
    bytes.extend_from_slice(&[b'P', b'K', 0x03, 0x04]);
    bytes.extend_from_slice(b"<script>fetch('/steal')</script>");
    bytes
}

pub fn pdf() -> Vec<u8> {
    b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n%%EOF\n".to_vec()
}

pub fn csv() -> Vec<u8> {
    b"email,name,plan\nann@example.com,Ann,pro\nbob@example.com,Bob,free\ncy@example.com,Cy,pro\n"
        .to_vec()
}

pub const EICAR: &[u8] =
    b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";
