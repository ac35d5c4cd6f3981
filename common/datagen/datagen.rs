//  Copyright (c) Facebook, Inc. and its affiliates.
//  SPDX-License-Identifier: Apache-2.0

use clap::App;
use clap::Arg;
use log::info;
use rand::distributions;
use rand::thread_rng;
use rand::Rng;

pub mod gen {
    use super::*;
    use rand::prelude::SliceRandom;
    use rayon::iter::IntoParallelIterator;
    use rayon::iter::ParallelIterator;

    /// One synthetic customer row: email, name, phone
    #[derive(Clone, Debug)]
    pub struct Person {
        pub email: String,
        pub name: String,
        pub phone: String,
    }

    pub struct Data {
        pub party_a: Vec<Person>,
        pub party_b: Vec<Person>,
    }

    /// Builds two datasets sharing `intersection_size` people.
    ///
    /// The copy of a shared person given to party b has its email upper-cased
    /// and padded, which matching must see through.
    pub fn random_data(party_a_size: usize, party_b_size: usize, intersection_size: usize) -> Data {
        let shared = par_random_people(intersection_size);
        let mut rng = rand::thread_rng();

        let mut party_a = par_random_people(party_a_size);
        party_a.extend_from_slice(&shared);
        party_a.shuffle(&mut rng);

        let mut party_b = par_random_people(party_b_size);
        party_b.extend(shared.into_iter().map(|p| Person {
            email: format!("  {} ", p.email.to_uppercase()),
            ..p
        }));
        party_b.shuffle(&mut rng);

        Data { party_a, party_b }
    }

    pub fn par_random_people(size: usize) -> Vec<Person> {
        (0..size)
            .into_par_iter()
            .map(|_| Person {
                email: format!("{}@example.com", random_string(12).to_lowercase()),
                name: random_string(8),
                phone: format!("555{:07}", thread_rng().gen_range(0..10_000_000u32)),
            })
            .collect::<Vec<Person>>()
    }

    /// Dummy alphanumeric string, for synthetic inputs only
    fn random_string(size: usize) -> String {
        thread_rng()
            .sample_iter(&distributions::Alphanumeric)
            .take(size)
            .map(char::from)
            .collect()
    }

    pub fn write_people_to_file(source: &[Person], path: &str) -> Result<(), csv::Error> {
        use indicatif::ProgressBar;

        let mut wr = csv::WriterBuilder::new()
            .buffer_capacity(1024)
            .from_path(path)?;
        wr.write_record(["email", "name", "phone"])?;
        let progress_bar = ProgressBar::new(source.len() as u64);
        for (i, p) in source.iter().enumerate() {
            wr.write_record([p.email.as_str(), p.name.as_str(), p.phone.as_str()])?;
            if i % 100 == 0 {
                progress_bar.inc(100);
            }
        }
        progress_bar.finish();
        wr.flush()?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let matches = App::new("PSI input generator")
        .version("0.1")
        .about("Generates two party CSV files with a known overlap")
        .arg(
            Arg::with_name("dir")
                .short("d")
                .long("dir")
                .value_name("DIR")
                .help("output dir")
                .takes_value(true)
                .default_value("./"),
        )
        .arg(
            Arg::with_name("size")
                .short("n")
                .long("size")
                .value_name("SIZE")
                .help("rows per party")
                .takes_value(true)
                .default_value("10"),
        )
        .arg(
            Arg::with_name("overlap")
                .short("o")
                .long("overlap")
                .value_name("OVERLAP")
                .help("rows shared by both parties")
                .takes_value(true)
                .default_value("5"),
        )
        .get_matches();

    let size = matches.value_of("size").unwrap_or("10").parse::<usize>()?;
    let overlap = matches
        .value_of("overlap")
        .unwrap_or("5")
        .parse::<usize>()?
        .min(size);
    let dir = matches.value_of("dir").unwrap_or("./");

    let fn_a = format!("{}/party_a_size_{}_overlap_{}.csv", dir, size, overlap);
    let fn_b = format!("{}/party_b_size_{}_overlap_{}.csv", dir, size, overlap);

    info!("Generating {} rows per party, {} shared", size, overlap);
    let data = gen::random_data(size - overlap, size - overlap, overlap);
    info!("Data generation done, writing to files");
    gen::write_people_to_file(&data.party_a, &fn_a)?;
    info!("File {} finished", fn_a);
    gen::write_people_to_file(&data.party_b, &fn_b)?;
    info!("File {} finished", fn_b);

    info!("Bye!");
    Ok(())
}
