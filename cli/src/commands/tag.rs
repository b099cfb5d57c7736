use anyhow::Result;

use foodgram_core::models::NewTag;
use foodgram_core::service::FoodgramService;

use super::helpers::print_tag_table;

pub(crate) fn cmd_tag_add(service: &FoodgramService, tag: &NewTag, json: bool) -> Result<()> {
    let tag = service.add_tag(tag)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tag)?);
    } else {
        println!("Added tag: {} ({}, id: {})", tag.name, tag.color, tag.id);
    }

    Ok(())
}

pub(crate) fn cmd_tag_list(service: &FoodgramService, json: bool) -> Result<()> {
    let tags = service.list_tags()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tags)?);
    } else if tags.is_empty() {
        eprintln!("No tags found");
    } else {
        print_tag_table(&tags);
    }

    Ok(())
}
