pub mod audio_file;
