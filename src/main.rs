use anyhow::Result;
use clap::Parser;
use evemu_play::lib_main::{lib_main_cli, Command, PlayArgs};

fn main() -> Result<()> {
    lib_main_cli(Command::Play(PlayArgs::parse()))
}
