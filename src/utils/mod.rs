pub mod convert;

pub mod file_io;

pub mod uri;

#[cfg(test)]
mod convert_test;


#[cfg(test)]
mod uri_test;
