fn main() {
    // The #[link] attribute in tflite.rs pulls in tensorflowlite_c; this only adds a
    // search path when the library lives outside the system default (cross images).
    println!("cargo:rerun-if-env-changed=TFLITE_LIB_DIR");
    if std::env::var_os("CARGO_FEATURE_VISION_TFLITE").is_none() {
        return;
    }
    if let Ok(dir) = std::env::var("TFLITE_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir);
    }
}
