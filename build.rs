#[cfg(windows)]
fn link_system_libs() {
    // only the static FFmpeg build pulls these in
    if std::env::var_os("CARGO_FEATURE_FFMPEG").is_none() {
        return;
    }
    println!("cargo:rustc-link-lib=Gdi32");
    println!("cargo:rustc-link-lib=OleAut32");
    println!("cargo:rustc-link-lib=Shlwapi");
    println!("cargo:rustc-link-lib=Mfuuid");
    println!("cargo:rustc-link-lib=Strmiids");
    println!("cargo:rustc-link-lib=Vfw32");
}

#[cfg(not(windows))]
fn link_system_libs() {}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    link_system_libs();
}
