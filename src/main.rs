use std::env;
use std::fs;
use std::io;
use std::process::exit;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use ckb_lab::address::{Address, AddressPayload};
use ckb_lab::describe::{describe_transaction, DescribeOptions};
use ckb_lab::hex::{bytes_to_hex, hex_to_bytes, hex_to_h256};
use ckb_lab::lab::{double_counter_step, Lab};
use ckb_lab::locks::{code_hash, data_lock, hash_lock_args};
use ckb_lab::signer::Secp256k1Signer;
use ckb_lab::{CellDep, Config, DepType, Error, HumanCapacity, OutPoint, Script, ScriptHashType};
use ckb_types::{bytes::Bytes, H256};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

fn version_string() -> String {
    format!("{} {}", env!("CARGO_PKG_VERSION"), env!("COMMIT_ID"))
}

fn ask_for_confirm(msg: &str) -> io::Result<bool> {
    println!("{} (Yes/No)", msg);
    let mut buf = String::new();
    io::stdin().read_line(&mut buf)?;
    Ok(["y", "yes"].contains(&buf.trim().to_lowercase().as_str()))
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.value_of("config") {
        Some(path) => Config::load(path).with_context(|| format!("load config {}", path))?,
        None => Config::default(),
    };
    if let Some(api) = matches.value_of("api") {
        config.node_url = api.to_string();
    }
    if let Some(fee) = matches.value_of("fee") {
        HumanCapacity::from_str(fee).map_err(|err| anyhow!("invalid fee {}: {}", fee, err))?;
        config.tx_fee = fee.to_string();
    }
    config.check()?;
    Ok(config)
}

fn load_signer(matches: &ArgMatches, config: &Config) -> Result<Secp256k1Signer> {
    let path = matches
        .value_of("privkey-path")
        .ok_or_else(|| anyhow!("--privkey-path is required for this command"))?;
    let content = fs::read_to_string(path).with_context(|| format!("read {}", path))?;
    let secret = hex_to_bytes(content.trim())?;
    Ok(Secp256k1Signer::new(&secret, &config.sighash)?)
}

fn parse_capacity(args: &ArgMatches, name: &str) -> Result<u64> {
    let value = args
        .value_of(name)
        .ok_or_else(|| anyhow!("missing --{}", name))?;
    Ok(HumanCapacity::from_str(value)?.into())
}

fn parse_h256(args: &ArgMatches, name: &str) -> Result<H256> {
    let value = args
        .value_of(name)
        .ok_or_else(|| anyhow!("missing --{}", name))?;
    Ok(H256(hex_to_h256(value)?))
}

/// The custom lock named by `--code-hash` and either `--args` or a hash
/// lock `--preimage`.
fn custom_lock(args: &ArgMatches) -> Result<(Script, Option<Bytes>)> {
    let code_hash = parse_h256(args, "code-hash")?;
    match (args.value_of("args"), args.value_of("preimage")) {
        (_, Some(preimage)) => {
            let preimage = Bytes::from(preimage.as_bytes().to_vec());
            Ok((data_lock(code_hash, hash_lock_args(&preimage)), Some(preimage)))
        }
        (Some(lock_args), None) => Ok((
            data_lock(code_hash, Bytes::from(hex_to_bytes(lock_args)?)),
            None,
        )),
        (None, None) => Ok((data_lock(code_hash, Bytes::new()), None)),
    }
}

fn parse_out_point(args: &ArgMatches, name: &str) -> Result<OutPoint> {
    let value = args
        .value_of(name)
        .ok_or_else(|| anyhow!("missing --{}", name))?;
    let (tx_hash, index) = value
        .split_once('#')
        .ok_or_else(|| anyhow!("invalid out point {}, expected <tx_hash>#<index>", value))?;
    Ok(OutPoint::new(
        H256(hex_to_h256(tx_hash)?),
        index
            .parse()
            .map_err(|err| anyhow!("invalid index {}: {}", index, err))?,
    ))
}

/// The type script named by `--type-code-hash` and `--type-args`, and the
/// dep loading its code from `--type-out-point`.
fn custom_type(args: &ArgMatches) -> Result<(Script, CellDep)> {
    let code_hash = parse_h256(args, "type-code-hash")?;
    let type_args = match args.value_of("type-args") {
        Some(type_args) => Bytes::from(hex_to_bytes(type_args)?),
        None => Bytes::new(),
    };
    let dep = CellDep::new(parse_out_point(args, "type-out-point")?, DepType::Code);
    Ok((Script::new(code_hash, ScriptHashType::Data, type_args), dep))
}

/// Print every draft and, unless `yes`, ask before it is signed.
fn open_lab(config: Config, yes: bool) -> Result<Lab> {
    let mut lab = Lab::new(config)?;
    lab.set_confirm(move |skeleton| {
        println!(
            "{}",
            describe_transaction(skeleton, &DescribeOptions::default())
        );
        Ok(yes || ask_for_confirm("Send this transaction?")?)
    });
    Ok(lab)
}

/// The receiver given by `--to`, the key's own lock otherwise.
fn receiver(args: &ArgMatches, matches: &ArgMatches, config: &Config) -> Result<Script> {
    match args.value_of("to") {
        Some(address) => Ok(Address::from_str(address)?.lock_script()),
        None => Ok(load_signer(matches, config)?.lock().clone()),
    }
}

fn run_cli() -> Result<()> {
    env_logger::init();

    let version = version_string();
    let code_args = [
        Arg::with_name("code-hash")
            .long("code-hash")
            .help("Data hash of the deployed lock code")
            .required(true)
            .takes_value(true),
        Arg::with_name("args")
            .long("args")
            .help("Lock args in hex")
            .takes_value(true),
        Arg::with_name("preimage")
            .long("preimage")
            .help("Hash lock preimage; the lock args become its blake2b hash")
            .conflicts_with("args")
            .takes_value(true),
    ];

    let type_args = [
        Arg::with_name("type-code-hash")
            .long("type-code-hash")
            .help("Data hash of the deployed type code")
            .required(true)
            .takes_value(true),
        Arg::with_name("type-args")
            .long("type-args")
            .help("Type script args in hex")
            .takes_value(true),
        Arg::with_name("type-out-point")
            .long("type-out-point")
            .help("Out point of the type code cell, <tx_hash>#<index>")
            .required(true)
            .takes_value(true),
    ];

    let app = App::new("ckb-lab")
        .setting(AppSettings::ArgRequiredElseHelp)
        .version(version.as_str())
        .author("Nervos Developer Tools Team")
        .about("Build, validate, sign and send CKB transactions")
        .args(&[
            Arg::with_name("config")
                .long("config")
                .short("c")
                .help("Path of lab.toml, testnet defaults when omitted")
                .global(true)
                .takes_value(true),
            Arg::with_name("privkey-path")
                .long("privkey-path")
                .help("File holding a hex secp256k1 private key")
                .global(true)
                .takes_value(true),
            Arg::with_name("api")
                .long("api")
                .help("CKB RPC url, overrides node_url")
                .global(true)
                .takes_value(true),
            Arg::with_name("fee")
                .long("fee")
                .help("Transaction fee in CKB, overrides tx_fee")
                .global(true)
                .takes_value(true),
            Arg::with_name("yes")
                .long("yes")
                .short("y")
                .help("Send without asking")
                .global(true),
        ])
        .subcommand(
            SubCommand::with_name("balance")
                .about("Show the capacity held by an address")
                .arg(
                    Arg::with_name("address")
                        .long("address")
                        .help("Address to query, the key's address when omitted")
                        .takes_value(true),
                )
                .display_order(0),
        )
        .subcommand(
            SubCommand::with_name("transfer")
                .about("Send capacity to an address")
                .args(&[
                    Arg::with_name("to")
                        .long("to")
                        .help("Receiver address")
                        .required(true)
                        .takes_value(true),
                    Arg::with_name("capacity")
                        .long("capacity")
                        .help("Capacity in CKB")
                        .required(true)
                        .takes_value(true),
                ])
                .display_order(1),
        )
        .subcommand(
            SubCommand::with_name("deploy")
                .about("Deploy a binary into a code cell")
                .args(&[
                    Arg::with_name("binary")
                        .long("binary")
                        .help("Path of the binary")
                        .required(true)
                        .takes_value(true),
                    Arg::with_name("type-id")
                        .long("type-id")
                        .help("Give the code cell a type id"),
                ])
                .display_order(2),
        )
        .subcommand(
            SubCommand::with_name("lock-cells")
                .about("Create cells under a custom lock")
                .args(&code_args)
                .args(&[
                    Arg::with_name("capacity")
                        .long("capacity")
                        .help("Capacity of each cell in CKB")
                        .default_value("100")
                        .takes_value(true),
                    Arg::with_name("count")
                        .long("count")
                        .help("Number of cells")
                        .default_value("1")
                        .takes_value(true),
                    Arg::with_name("data")
                        .long("data")
                        .help("Cell data in hex")
                        .takes_value(true),
                ])
                .display_order(3),
        )
        .subcommand(
            SubCommand::with_name("unlock-cells")
                .about("Consume every cell under a custom lock")
                .args(&code_args)
                .args(&[
                    Arg::with_name("code-out-point")
                        .long("code-out-point")
                        .help("Out point of the lock code cell, <tx_hash>#<index>")
                        .required(true)
                        .takes_value(true),
                    Arg::with_name("to")
                        .long("to")
                        .help("Receiver address, the key's address when omitted")
                        .takes_value(true),
                ])
                .display_order(4),
        )
        .subcommand(
            SubCommand::with_name("hash")
                .about("Print the data hash and hash lock args of a file or text")
                .args(&[
                    Arg::with_name("file")
                        .long("file")
                        .help("File to hash")
                        .takes_value(true),
                    Arg::with_name("text")
                        .long("text")
                        .help("Text to hash")
                        .conflicts_with("file")
                        .takes_value(true),
                ])
                .display_order(5),
        )
        .subcommand(
            SubCommand::with_name("create-type-cells")
                .about("Create cells of the key's lock typed by deployed code")
                .args(&type_args)
                .args(&[
                    Arg::with_name("capacity")
                        .long("capacity")
                        .help("Capacity of each cell in CKB")
                        .required(true)
                        .takes_value(true),
                    Arg::with_name("data")
                        .long("data")
                        .help("Data of one cell in hex, repeat for more cells")
                        .required(true)
                        .multiple(true)
                        .number_of_values(1)
                        .takes_value(true),
                ])
                .display_order(6),
        )
        .subcommand(
            SubCommand::with_name("update-counters")
                .about("Step every double counter cell of the key: +1 and +2")
                .args(&type_args)
                .display_order(7),
        )
        .subcommand(
            SubCommand::with_name("consume-type-cells")
                .about("Consume every cell of the key typed by deployed code")
                .args(&type_args)
                .arg(
                    Arg::with_name("to")
                        .long("to")
                        .help("Receiver address, the key's address when omitted")
                        .takes_value(true),
                )
                .display_order(8),
        );

    let matches = app.get_matches();
    let yes = matches.is_present("yes");
    match matches.subcommand() {
        ("hash", Some(args)) => {
            let data = match (args.value_of("file"), args.value_of("text")) {
                (Some(path), _) => fs::read(path).with_context(|| format!("read {}", path))?,
                (None, Some(text)) => text.as_bytes().to_vec(),
                (None, None) => return Err(anyhow!("one of --file or --text is required")),
            };
            println!("data hash: {:#x}", code_hash(&data));
            println!("hash lock args: {}", bytes_to_hex(&hash_lock_args(&data)));
        }
        ("balance", Some(args)) => {
            let config = load_config(&matches)?;
            let lock = match args.value_of("address") {
                Some(address) => Address::from_str(address)?.lock_script(),
                None => load_signer(&matches, &config)?.lock().clone(),
            };
            let lab = Lab::new(config)?;
            let capacity = lab.balance(&lock)?;
            let address = Address::new(lab.config().network, AddressPayload::short_or_full(&lock));
            match u64::try_from(capacity) {
                Ok(capacity) => println!("{}: {:#}", address, HumanCapacity(capacity)),
                Err(_) => println!("{}: {} shannons", address, capacity),
            }
        }
        ("transfer", Some(args)) => {
            let config = load_config(&matches)?;
            let signer = load_signer(&matches, &config)?;
            let to = Address::from_str(args.value_of("to").unwrap_or_default())?.lock_script();
            let capacity = parse_capacity(args, "capacity")?;
            let mut lab = open_lab(config, yes)?;
            let tx_hash = lab.transfer(&signer, signer.lock(), to, capacity)?;
            println!("Committed {:#x}", tx_hash);
        }
        ("deploy", Some(args)) => {
            let config = load_config(&matches)?;
            let signer = load_signer(&matches, &config)?;
            let path = args.value_of("binary").unwrap_or_default();
            let binary = Bytes::from(fs::read(path).with_context(|| format!("read {}", path))?);
            let mut lab = open_lab(config, yes)?;
            let deployed =
                lab.deploy_code(binary, &signer, signer.lock(), args.is_present("type-id"))?;
            println!("out point: {}", deployed.out_point);
            println!("data hash: {:#x}", deployed.data_hash);
            if let Some(type_id) = &deployed.type_id {
                println!("type id hash: {:#x}", type_id.hash());
            }
        }
        ("lock-cells", Some(args)) => {
            let config = load_config(&matches)?;
            let signer = load_signer(&matches, &config)?;
            let (lock, _) = custom_lock(args)?;
            let capacity = parse_capacity(args, "capacity")?;
            let count: usize = args
                .value_of("count")
                .unwrap_or("1")
                .parse()
                .map_err(|err| anyhow!("invalid --count: {}", err))?;
            let data = match args.value_of("data") {
                Some(data) => Bytes::from(hex_to_bytes(data)?),
                None => Bytes::new(),
            };
            let mut lab = open_lab(config, yes)?;
            let tx_hash = lab.lock_cells(&signer, signer.lock(), &lock, capacity, count, data)?;
            println!("Committed {:#x}", tx_hash);
        }
        ("unlock-cells", Some(args)) => {
            let config = load_config(&matches)?;
            let (lock, preimage) = custom_lock(args)?;
            let code_dep = CellDep::new(parse_out_point(args, "code-out-point")?, DepType::Code);
            let receiver = receiver(args, &matches, &config)?;
            // the hash lock hashes the raw witness
            let witnesses: Vec<Bytes> = preimage.into_iter().collect();
            let mut lab = open_lab(config, yes)?;
            let tx_hash = lab.unlock_cells(code_dep, &lock, witnesses, receiver)?;
            println!("Committed {:#x}", tx_hash);
        }
        ("create-type-cells", Some(args)) => {
            let config = load_config(&matches)?;
            let signer = load_signer(&matches, &config)?;
            let (type_script, type_dep) = custom_type(args)?;
            let capacity = parse_capacity(args, "capacity")?;
            let data = args
                .values_of("data")
                .into_iter()
                .flatten()
                .map(|data| Ok(Bytes::from(hex_to_bytes(data)?)))
                .collect::<Result<Vec<Bytes>>>()?;
            let mut lab = open_lab(config, yes)?;
            let tx_hash = lab.create_type_cells(
                &signer,
                signer.lock(),
                &type_script,
                type_dep,
                capacity,
                data,
            )?;
            println!("Committed {:#x}", tx_hash);
        }
        ("update-counters", Some(args)) => {
            let config = load_config(&matches)?;
            let signer = load_signer(&matches, &config)?;
            let (type_script, type_dep) = custom_type(args)?;
            let mut lab = open_lab(config, yes)?;
            let tx_hash = lab.update_type_cells(
                &signer,
                signer.lock(),
                &type_script,
                type_dep,
                double_counter_step,
            )?;
            println!("Committed {:#x}", tx_hash);
        }
        ("consume-type-cells", Some(args)) => {
            let config = load_config(&matches)?;
            let signer = load_signer(&matches, &config)?;
            let (type_script, type_dep) = custom_type(args)?;
            let receiver = receiver(args, &matches, &config)?;
            let mut lab = open_lab(config, yes)?;
            let tx_hash =
                lab.consume_type_cells(&signer, signer.lock(), &type_script, type_dep, receiver)?;
            println!("Committed {:#x}", tx_hash);
        }
        (command, _) => {
            eprintln!("unrecognize command '{}'", command);
            eprintln!("{}", matches.usage());
            exit(1);
        }
    }
    Ok(())
}

fn main() {
    let backtrace_level = env::var("RUST_BACKTRACE").unwrap_or_default();
    let enable_backtrace = !backtrace_level.is_empty() && backtrace_level != "0";
    match run_cli() {
        Ok(_) => {}
        Err(err) if matches!(err.downcast_ref::<Error>(), Some(Error::Cancelled)) => {
            println!("Cancelled");
        }
        Err(err) if enable_backtrace => {
            eprintln!("error: {:?}", err);
            exit(-1);
        }
        Err(err) => {
            eprintln!("error: {}", err);
            exit(-1);
        }
    }
}
