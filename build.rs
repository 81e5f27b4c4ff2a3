#[cfg(windows)]
fn main() {
    use winres::WindowsResource;

    WindowsResource::new()
        .set("ProductName", "Superscale")
        .set("FileDescription", "Neural super-resolution image upscaler")
        .set("LegalCopyright", "Copyright (C) 2026")
        .compile()
        .unwrap();
}

#[cfg(not(windows))]
fn main() {
    // Nothing to do on non-Windows platforms
}
