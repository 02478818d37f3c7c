//! Province catalog - the selectable starting regions, 1520 borders

/// Full catalog of selectable provinces. A room member claims at most one,
/// and no two members of the same room may hold the same entry.
pub const PROVINCES: &[&str] = &[
    // Anatolian provinces
    "Rum",
    "Anatolia",
    "Karaman",
    "Dulkadir",
    "Diyarbekir",
    "Trebizond",
    // Anatolian sanjaks
    "Kastamonu",
    "Bolu",
    "Hudavendigar",
    "Karesi",
    "Saruhan",
    "Aydin",
    "Menteshe",
    "Teke",
    "Hamid",
    // Balkan provinces
    "Rumelia",
    // Balkan sanjaks
    "Salonica",
    "Morea",
    "Yanina",
    "Ohrid",
    "Uskup",
    "Kosovo",
    "Smederevo",
    "Vidin",
    "Nicopolis",
    "Silistra",
    "Bosnia",
    "Herzegovina",
    "Albania",
    // Middle East
    "Aleppo",
    "Damascus",
    "Raqqa",
    "Mosul",
    // Africa
    "Egypt",
    "Tripolitania",
    "Algiers",
    // Vassal states
    "Crimea",
    "Wallachia",
    "Moldavia",
    "Transylvania",
    "Ragusa",
    // Neighboring powers (playable)
    "Safavid Empire",
    "Kingdom of Hungary",
    "Venice",
    "Poland-Lithuania",
];
