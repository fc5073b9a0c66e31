fn main() {
    std::process::exit(slitcam_lib::run())
}
