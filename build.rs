fn main() {
    // ESP-IDF link arguments are only needed for the on-device binary.
    // Host builds (tests, fuzzing) compile without the `espidf` feature.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
